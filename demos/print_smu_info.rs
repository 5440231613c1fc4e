use tracing_subscriber::EnvFilter;
use zen_smu::smu::mailbox::MailboxKind;
use zen_smu::smu::power_table::Field;
use zen_smu::{Cpu, CpuStatus, SmuConfig, SmuStatus};

fn print_topology(cpu: &Cpu) {
    let Some(topology) = cpu.topology() else {
        println!("  (topology unavailable)");
        return;
    };

    println!(
        "  Cores: {} ({} threads each), CCDs: {}, CCXs: {}",
        topology.cores, topology.threads_per_core, topology.ccds, topology.ccxs
    );
    println!(
        "  CCD enable map: {:#04x}, core disable map: {:#018x}",
        topology.ccd_enable_map, topology.core_disable_map
    );

    for index in 0..topology.cores {
        let (Some(address), Some(mask)) = (topology.core_address(index), topology.core_mask(index))
        else {
            continue;
        };
        let perf = topology
            .performance
            .get(index as usize)
            .copied()
            .unwrap_or(0);
        println!(
            "  - Core {index:>2}: CCD{} CCX{} #{} mask {mask:#010x} APIC {:>3} perf {perf}",
            address.ccd,
            address.ccx,
            address.core,
            topology.apic_id(index).unwrap_or(0),
        );
    }

    for issue in &topology.issues {
        println!("  ! {issue:?}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    println!("--- AMD SMU Information ---");

    let cpu = match Cpu::open(SmuConfig::from_env()) {
        Ok(cpu) => cpu,
        Err(e) => {
            eprintln!("Could not open the SMU (running as root on an AMD Zen CPU?): {e}");
            return Err(e.into());
        }
    };

    let identity = cpu.identity();
    println!(
        "Family {:#x} Model {:#x} Stepping {:#x} ({:?})",
        identity.signature.family,
        identity.signature.model,
        identity.signature.stepping,
        identity.signature.package
    );
    println!("Codename:      {:?}", identity.codename);
    println!("SMU type:      {:?}", identity.smu_type());
    println!("SMU version:   {:#010x}", identity.smu_version);
    println!("Table version: {:#x}", identity.table_version);
    println!("HSMP version:  {}", cpu.hsmp_version());
    if let Some(patch) = cpu.patch_level() {
        println!("Patch level:   {patch:#x}");
    }
    println!(
        "Test message:  RSMU {} / MP1 {}",
        cpu.send_test_message(MailboxKind::Rsmu),
        cpu.send_test_message(MailboxKind::Mp1)
    );

    if cpu.status() == CpuStatus::PartiallyInitialized {
        println!(
            "Partially initialized: {}",
            cpu.last_error().map_or_else(|| "unknown".to_string(), ToString::to_string)
        );
    }

    println!("\n--- Topology ---");
    print_topology(&cpu);

    println!("\n--- Power Table ---");
    match cpu.refresh_power_table() {
        SmuStatus::Ok => {
            if let Some(snapshot) = cpu.snapshot() {
                for field in Field::ALL {
                    if let Some(value) = snapshot.get(field) {
                        println!("  {:<14} {value:>10.3}", field.name());
                    }
                }
            }
        }
        status => println!("  refresh failed: {status}"),
    }

    println!("\nOC mode: {}", cpu.oc_mode());
    if let Some(scalar) = cpu.pbo_scalar() {
        println!("PBO scalar: {scalar}");
    }

    if cpu.hsmp_version() > 0 {
        println!("\n--- HSMP ---");
        if let Some(watts) = cpu.socket_power() {
            println!("Socket power:  {watts:.1} W");
        }
        if let Some((fclk, memclk)) = cpu.fclk_memclk() {
            println!("FCLK/MEMCLK:   {fclk}/{memclk} MHz");
        }
        if let Some(limit) = cpu.cclk_frequency_limit() {
            println!("CCLK limit:    {limit} MHz");
        }
        if let Some(residency) = cpu.socket_c0_residency() {
            println!("C0 residency:  {residency}%");
        }
        if let Some(prochot) = cpu.prochot_asserted() {
            println!("PROCHOT:       {prochot}");
        }
        if let Some(bw) = cpu.ddr_bandwidth() {
            println!(
                "DDR bandwidth: {}/{} GB/s ({}%)",
                bw.utilized_gbps, bw.max_gbps, bw.utilized_percent
            );
        }
    }

    Ok(())
}
