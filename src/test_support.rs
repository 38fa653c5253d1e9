//! Helpers shared by unit tests.

use std::path::{Path, PathBuf};

/// Write an executable shell script standing in for an external tool.
pub fn create_test_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    let script_path = dir.join(name);
    std::fs::write(&script_path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();
    }
    script_path
}

/// Create `<dir>/<name>.yml` with a trivial play.
pub fn write_playbook(dir: &Path, name: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join(format!("{name}.yml")),
        "- hosts: localhost\n  tasks: []\n",
    )
    .unwrap();
}
