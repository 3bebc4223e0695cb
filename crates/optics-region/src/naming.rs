use std::path::{Path, PathBuf};

/// Prefix every region's backing OS object name carries.
pub const OBJECT_PREFIX: &str = "optics.";

/// Default shared-memory directory on platforms that have one.
const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// Resolves the directory backing regions live in. Overridable via
/// `OPTICS_SHM_DIR` so tests (and non-Linux hosts) can redirect region
/// files to a scratch directory without touching a real `/dev/shm`.
pub fn shm_dir() -> PathBuf {
    std::env::var_os("OPTICS_SHM_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SHM_DIR))
}

/// Maps a logical region name to its full backing-object path.
pub fn object_path(name: &str) -> PathBuf {
    shm_dir().join(format!("{OBJECT_PREFIX}{name}"))
}

/// Extracts the logical name from a backing-object file name, if it carries
/// the `optics.` prefix.
pub fn logical_name(file_name: &str) -> Option<&str> {
    file_name.strip_prefix(OBJECT_PREFIX)
}

/// Enumerates the logical names of every region currently backed by an
/// object under the shared-memory directory. This is the host-enumeration
/// step the poller drives through a narrower trait; it is exposed here too
/// since it is naturally a region-naming concern.
pub fn list_region_names() -> std::io::Result<Vec<String>> {
    list_region_names_in(&shm_dir())
}

pub fn list_region_names_in(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        if let Some(file_name) = entry.file_name().to_str() {
            if let Some(logical) = logical_name(file_name) {
                names.push(logical.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Removes every region's backing object under the shared-memory directory.
pub fn unlink_all() -> std::io::Result<()> {
    for name in list_region_names()? {
        let _ = std::fs::remove_file(object_path(&name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_applies_prefix() {
        let path = object_path("t1");
        assert!(path.to_string_lossy().ends_with("optics.t1"));
    }

    #[test]
    fn logical_name_strips_prefix_only_when_present() {
        assert_eq!(logical_name("optics.t1"), Some("t1"));
        assert_eq!(logical_name("not-optics"), None);
    }

    #[test]
    fn list_region_names_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("optics.b"), b"").unwrap();
        std::fs::write(dir.path().join("optics.a"), b"").unwrap();
        std::fs::write(dir.path().join("unrelated"), b"").unwrap();
        let names = list_region_names_in(dir.path()).unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
