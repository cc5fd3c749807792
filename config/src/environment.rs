//! Environment handed to the installer.
//!
//! The installer starts with a fixed, cleared environment. Only `TERM`
//! varies at runtime (it depends on the elected console) and the library
//! path depends on the platform word size.

/// Search path including the target system and driver update directories.
const PATH: &str = "/usr/bin:/bin:/sbin:/usr/sbin:/mnt/sysimage/bin:\
/mnt/sysimage/usr/bin:/mnt/sysimage/usr/sbin:/mnt/sysimage/sbin:\
/mnt/sysimage/usr/X11R6/bin:\
/tmp/DD/bin:/tmp/DD/sbin:/tmp/DD/usr/bin:/tmp/DD/usr/sbin";

const LD_LIBRARY_PATH_64: &str =
    "/lib64:/usr/lib64:/lib:/usr/lib:/tmp/DD/lib64:/tmp/DD/usr/lib64:/tmp/DD/lib:/tmp/DD/usr/lib";

const LD_LIBRARY_PATH_32: &str = "/lib:/usr/lib:/tmp/DD/lib:/tmp/DD/usr/lib";

/// Terminal type used until a console says otherwise.
pub const DEFAULT_TERM: &str = "linux";

/// Build the installer environment, in order.
pub fn installer_environment(lib64: bool, term: &str) -> Vec<(&'static str, String)> {
    let ld_library_path = if lib64 {
        LD_LIBRARY_PATH_64
    } else {
        LD_LIBRARY_PATH_32
    };

    vec![
        ("PATH", PATH.to_string()),
        ("LD_LIBRARY_PATH", ld_library_path.to_string()),
        ("HOME", "/".to_string()),
        ("TERM", term.to_string()),
        ("DEBUG", String::new()),
        ("TERMINFO", "/etc/linux-terminfo".to_string()),
        ("PYTHONPATH", "/tmp/updates".to_string()),
        ("MALLOC_CHECK_", "2".to_string()),
        ("MALLOC_PERTURB_", "204".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(env: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        env.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_term_is_substituted() {
        let env = installer_environment(true, "vt100-nav");
        assert_eq!(lookup(&env, "TERM"), Some("vt100-nav"));
        assert_eq!(lookup(&env, "HOME"), Some("/"));
        assert_eq!(lookup(&env, "DEBUG"), Some(""));
    }

    #[test]
    fn test_library_path_width() {
        let env64 = installer_environment(true, DEFAULT_TERM);
        let env32 = installer_environment(false, DEFAULT_TERM);

        assert!(lookup(&env64, "LD_LIBRARY_PATH").is_some_and(|p| p.starts_with("/lib64:")));
        assert!(lookup(&env32, "LD_LIBRARY_PATH").is_some_and(|p| !p.contains("lib64")));
    }

    #[test]
    fn test_path_includes_driver_updates() {
        let env = installer_environment(false, DEFAULT_TERM);
        let path = lookup(&env, "PATH").unwrap_or_default();
        assert!(path.contains("/tmp/DD/bin"));
        assert!(path.contains("/mnt/sysimage/usr/sbin"));
    }
}
