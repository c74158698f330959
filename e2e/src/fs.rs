//! Filesystem helpers run on a test instance. Tests use these to check what
//! the driver actually mounted and wrote.

use tracing::warn;

use crate::error::{Error, Result};
use crate::remote::RemoteInstance;

const GIB: i64 = 1024 * 1024 * 1024;

pub fn bytes_to_gb(bytes: i64) -> i64 {
    bytes / GIB
}

/// Recursively chmods `path` with a zero umask, restoring the user's umask
/// afterwards.
pub async fn force_chmod(instance: &dyn RemoteInstance, path: &str, perms: &str) -> Result<()> {
    let original = instance
        .ssh_no_sudo(&["umask"])
        .await
        .map_err(|e| Error::remote("failed to umask", e))?;
    let original = original.trim();

    instance
        .ssh_no_sudo(&["umask", "0000"])
        .await
        .map_err(|e| Error::remote("failed to umask", e))?;

    let chmod = instance.ssh(&["chmod", "-R", perms, path]).await;

    let restore = instance.ssh_no_sudo(&["umask", original]).await;
    if let Err(e) = chmod {
        if let Err(restore_err) = restore {
            warn!("failed to restore umask {} after chmod failure: {}", original, restore_err);
        }
        return Err(Error::remote(format!("failed to chmod file {path}"), e));
    }
    restore.map_err(|e| Error::remote("failed to umask", e))?;
    Ok(())
}

/// Writes `contents` to `path` with `echo contents > path`.
///
/// `contents` reaches the remote shell unquoted, so it is word-split and
/// glob-expanded there. Pass plain words only.
pub async fn write_file(instance: &dyn RemoteInstance, path: &str, contents: &str) -> Result<()> {
    instance
        .ssh_no_sudo(&["echo", contents, ">", path])
        .await
        .map_err(|e| Error::remote(format!("failed to write test file {path}"), e))?;
    Ok(())
}

pub async fn read_file(instance: &dyn RemoteInstance, path: &str) -> Result<String> {
    instance
        .ssh_no_sudo(&["cat", path])
        .await
        .map_err(|e| Error::remote(format!("failed to read test file {path}"), e))
}

/// Size of the filesystem mounted at `mount_path`, in GiB as reported by `df`.
pub async fn fs_size_gb(instance: &dyn RemoteInstance, mount_path: &str) -> Result<i64> {
    let output = instance
        .ssh_no_sudo(&["df", "--output=size", "-BG", mount_path, "|", "awk", "'NR==2'"])
        .await
        .map_err(|e| Error::remote(format!("failed to get size of path {mount_path}"), e))?;
    parse_df_size(&output)
}

/// Size of the block device at `device_path`, in whole GiB.
pub async fn block_size_gb(instance: &dyn RemoteInstance, device_path: &str) -> Result<i64> {
    let output = instance
        .ssh(&["blockdev", "--getsize64", device_path])
        .await
        .map_err(|e| Error::remote(format!("failed to get size of path {device_path}"), e))?;
    let bytes = parse_int(output.trim())?;
    Ok(bytes_to_gb(bytes))
}

pub async fn rm_all(instance: &dyn RemoteInstance, path: &str) -> Result<()> {
    instance
        .ssh(&["rm", "-rf", path])
        .await
        .map_err(|e| Error::remote(format!("failed to delete all {path}"), e))?;
    Ok(())
}

/// Parses a `df -BG` size cell such as `"  10G\n"`.
pub fn parse_df_size(output: &str) -> Result<i64> {
    let trimmed = output.trim();
    parse_int(trimmed.strip_suffix('G').unwrap_or(trimmed))
}

fn parse_int(s: &str) -> Result<i64> {
    s.parse().map_err(|_| Error::Parse { input: s.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bytes_to_gb_truncates() {
        assert_eq!(bytes_to_gb(0), 0);
        assert_eq!(bytes_to_gb(GIB - 1), 0);
        assert_eq!(bytes_to_gb(10 * GIB), 10);
        assert_eq!(bytes_to_gb(10 * GIB + 512), 10);
    }

    #[test]
    fn test_parse_df_size() {
        assert_eq!(parse_df_size("   10G\n").unwrap(), 10);
        assert_eq!(parse_df_size("7").unwrap(), 7);
        assert!(matches!(parse_df_size("Size\n"), Err(Error::Parse { .. })));
        assert!(parse_df_size("").is_err());
    }

    proptest! {
        #[test]
        fn padded_df_cells_parse(n in 0i64..1_000_000, lead in 0usize..8) {
            let cell = format!("{}{}G\n", " ".repeat(lead), n);
            prop_assert_eq!(parse_df_size(&cell).unwrap(), n);
        }
    }
}
