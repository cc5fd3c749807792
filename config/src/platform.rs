//! Per-architecture profiles.
//!
//! Console probing and the installer's library path differ between
//! architectures. Rather than branching at compile time throughout the init,
//! the differences live in one table keyed by [`Platform`], resolved once at
//! startup.

/// Target platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// 32-bit x86
    X86,
    /// x86_64
    X86_64,
    /// 32-bit POWER
    PowerPc,
    /// 64-bit POWER
    PowerPc64,
    /// IBM System z
    S390x,
    /// SPARC
    Sparc64,
    /// Anything else
    Other,
}

/// Behaviour that depends on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformProfile {
    /// Hypervisor/management consoles probed in order before falling back
    pub console_candidates: &'static [&'static str],
    /// Whether baud rates take part in the console mode comparison
    pub compare_speed: bool,
    /// Whether the init probes and configures a console at all
    pub manages_console: bool,
    /// Whether a fatal error spins forever instead of continuing
    pub spins_on_fatal: bool,
    /// Whether the installer gets the 64-bit library search path
    pub lib64: bool,
}

const X86_CONSOLES: &[&str] = &["/dev/xvc0", "/dev/hvc0"];
const POWERPC_CONSOLES: &[&str] = &["/dev/hvc0", "/dev/hvsi0", "/dev/hvsi1", "/dev/hvsi2"];

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_arch = "x86_64") {
            Platform::X86_64
        } else if cfg!(target_arch = "x86") {
            Platform::X86
        } else if cfg!(target_arch = "powerpc64") {
            Platform::PowerPc64
        } else if cfg!(target_arch = "powerpc") {
            Platform::PowerPc
        } else if cfg!(target_arch = "s390x") {
            Platform::S390x
        } else if cfg!(target_arch = "sparc64") {
            Platform::Sparc64
        } else {
            Platform::Other
        }
    }

    /// Look up the profile for this platform.
    pub fn profile(self) -> PlatformProfile {
        match self {
            Platform::X86 => PlatformProfile {
                console_candidates: X86_CONSOLES,
                compare_speed: true,
                manages_console: true,
                spins_on_fatal: true,
                lib64: false,
            },
            Platform::X86_64 => PlatformProfile {
                console_candidates: X86_CONSOLES,
                compare_speed: true,
                manages_console: true,
                spins_on_fatal: true,
                lib64: true,
            },
            Platform::PowerPc => PlatformProfile {
                console_candidates: POWERPC_CONSOLES,
                compare_speed: true,
                manages_console: true,
                spins_on_fatal: true,
                lib64: false,
            },
            Platform::PowerPc64 => PlatformProfile {
                console_candidates: POWERPC_CONSOLES,
                compare_speed: true,
                manages_console: true,
                spins_on_fatal: true,
                lib64: true,
            },
            Platform::S390x => PlatformProfile {
                console_candidates: &[],
                compare_speed: false,
                manages_console: false,
                spins_on_fatal: false,
                lib64: true,
            },
            Platform::Sparc64 => PlatformProfile {
                console_candidates: &[],
                compare_speed: false,
                manages_console: true,
                spins_on_fatal: true,
                lib64: false,
            },
            Platform::Other => PlatformProfile {
                console_candidates: &[],
                compare_speed: true,
                manages_console: true,
                spins_on_fatal: true,
                lib64: false,
            },
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::X86 => write!(f, "x86"),
            Platform::X86_64 => write!(f, "x86_64"),
            Platform::PowerPc => write!(f, "ppc"),
            Platform::PowerPc64 => write!(f, "ppc64"),
            Platform::S390x => write!(f, "s390x"),
            Platform::Sparc64 => write!(f, "sparc64"),
            Platform::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s390_skips_console() {
        let profile = Platform::S390x.profile();
        assert!(!profile.manages_console);
        assert!(!profile.spins_on_fatal);
        assert!(profile.console_candidates.is_empty());
    }

    #[test]
    fn test_powerpc_candidate_order() {
        let profile = Platform::PowerPc64.profile();
        assert_eq!(profile.console_candidates.first(), Some(&"/dev/hvc0"));
        assert_eq!(profile.console_candidates.len(), 4);
    }

    #[test]
    fn test_sparc_ignores_speed() {
        assert!(!Platform::Sparc64.profile().compare_speed);
        assert!(Platform::X86_64.profile().compare_speed);
    }

    #[test]
    fn test_current_is_stable() {
        assert_eq!(Platform::current(), Platform::current());
        assert_eq!(Platform::current().profile(), Platform::current().profile());
    }
}
