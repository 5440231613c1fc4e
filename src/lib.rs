//! Access to the System Management Unit of AMD Zen processors.
//!
//! The crate identifies the processor, talks to its SMU mailboxes (RSMU, MP1 and
//! HSMP) through the SMN register window, reads the firmware power table from
//! DRAM and resolves the core topology needed to address individual cores.
//!
//! ```no_run
//! use zen_smu::{Cpu, SmuConfig};
//!
//! let cpu = Cpu::open(SmuConfig::from_env())?;
//! println!("{:?} SMU {:#x}", cpu.codename(), cpu.smu_version());
//! cpu.refresh_power_table();
//! # Ok::<(), zen_smu::SmuError>(())
//! ```

pub mod config;
pub mod cpu;
pub mod error;
pub mod hw;
pub mod smu;
pub mod utils;

pub use config::SmuConfig;
pub use cpu::{Cpu, CpuStatus};
pub use error::{SmuError, SmuResult};
pub use smu::mailbox::SmuStatus;
