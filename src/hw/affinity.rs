use std::io;
use std::mem;
use tracing::warn;

/// A set of logical processors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuMask {
    words: Vec<u64>,
}

impl CpuMask {
    #[must_use]
    pub fn single(cpu: usize) -> Self {
        let mut mask = Self::default();
        mask.insert(cpu);
        mask
    }

    pub fn insert(&mut self, cpu: usize) {
        let word = cpu / 64;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (cpu % 64);
    }

    #[must_use]
    pub fn contains(&self, cpu: usize) -> bool {
        self.words
            .get(cpu / 64)
            .is_some_and(|word| word & (1 << (cpu % 64)) != 0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..64).filter(move |bit| word & (1 << bit) != 0).map(move |bit| i * 64 + bit)
        })
    }

    /// Lowest processor in the set.
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }
}

impl FromIterator<usize> for CpuMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut mask = Self::default();
        for cpu in iter {
            mask.insert(cpu);
        }
        mask
    }
}

/// Reads and sets the processor affinity of the calling thread.
pub trait AffinityControl: Send + Sync {
    fn current(&self) -> io::Result<CpuMask>;

    fn apply(&self, mask: &CpuMask) -> io::Result<()>;
}

/// Pins the calling thread and restores the previous affinity when dropped.
///
/// Restoration happens on every exit path, including early returns and panics
/// during enumeration.
pub struct PinGuard<'a> {
    control: &'a dyn AffinityControl,
    saved: CpuMask,
}

impl<'a> PinGuard<'a> {
    /// Saves the current affinity and pins the thread to `cpu`.
    pub fn pin(control: &'a dyn AffinityControl, cpu: usize) -> io::Result<Self> {
        let saved = control.current()?;
        control.apply(&CpuMask::single(cpu))?;
        Ok(Self { control, saved })
    }

    /// Moves the thread to another processor, keeping the originally saved affinity.
    pub fn repin(&self, cpu: usize) -> io::Result<()> {
        self.control.apply(&CpuMask::single(cpu))
    }

    #[must_use]
    pub fn saved(&self) -> &CpuMask {
        &self.saved
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.control.apply(&self.saved) {
            warn!("Failed to restore thread affinity: {e}");
        }
    }
}

/// `sched_getaffinity`/`sched_setaffinity` on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxAffinity;

impl AffinityControl for LinuxAffinity {
    fn current(&self) -> io::Result<CpuMask> {
        // SAFETY: cpu_set_t is a plain bitmap, all-zero is a valid empty set.
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        // SAFETY: `set` is a valid, writable cpu_set_t of the size we pass.
        let ret =
            unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let max = usize::try_from(libc::CPU_SETSIZE).unwrap_or(1024);
        // SAFETY: CPU_ISSET only reads the bitmap and `cpu` is below CPU_SETSIZE.
        Ok((0..max)
            .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) })
            .collect())
    }

    fn apply(&self, mask: &CpuMask) -> io::Result<()> {
        // SAFETY: see `current`.
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        let max = usize::try_from(libc::CPU_SETSIZE).unwrap_or(1024);
        for cpu in mask.iter().take_while(|&cpu| cpu < max) {
            // SAFETY: `cpu` is below CPU_SETSIZE.
            unsafe { libc::CPU_SET(cpu, &mut set) };
        }

        // SAFETY: `set` is a valid cpu_set_t of the size we pass.
        let ret = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
