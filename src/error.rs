use crate::smu::mailbox::SmuStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmuError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported CPU vendor: {0}")]
    NotAmd(String),

    #[error("CPU identification failed: {0}")]
    Identification(String),

    #[error("Could not get DRAM base address")]
    DramBaseAddressZero,

    #[error("SMU command {operation} failed with status {status:?}")]
    Command {
        operation: &'static str,
        status: SmuStatus,
    },

    #[error("Topology detection failed: {0}")]
    Topology(String),

    #[error("Core layout probe exhausted on CCD{ccd} after {probes} probes")]
    ProbeExhausted { ccd: u32, probes: u32 },

    #[error("Invalid core index: {index} (have {count} cores)")]
    InvalidCore { index: u32, count: u32 },
}

// A convenient alias
pub type SmuResult<T> = Result<T, SmuError>;
