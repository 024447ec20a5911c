//! 9p mount command rendering.
//!
//! Commands are composed here and executed elsewhere over SSH.

use std::net::IpAddr;

/// Default 9p protocol version.
pub const DEFAULT_9P_VERSION: &str = "9p2000.L";

/// Default 9p message size in bytes.
pub const DEFAULT_MSIZE: u32 = 262144;

/// uid/gid of the `docker` user on devvm guest images.
pub const DEFAULT_MOUNT_ID: u32 = 1001;

/// Caller-supplied parameters of a guest mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Mount point inside the guest
    pub path: String,
    /// TCP port of the 9p server on the host
    pub port: u16,
    /// 9p protocol version
    pub version: String,
    pub uid: u32,
    pub gid: u32,
    pub msize: u32,
}

impl MountOptions {
    pub fn new(path: impl Into<String>, port: u16) -> Self {
        Self {
            path: path.into(),
            port,
            version: DEFAULT_9P_VERSION.to_string(),
            uid: DEFAULT_MOUNT_ID,
            gid: DEFAULT_MOUNT_ID,
            msize: DEFAULT_MSIZE,
        }
    }
}

/// A fully resolved 9p mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub ip: IpAddr,
    pub path: String,
    pub port: u16,
    pub version: String,
    pub uid: u32,
    pub gid: u32,
    pub msize: u32,
}

impl MountSpec {
    pub fn new(ip: IpAddr, options: &MountOptions) -> Self {
        Self {
            ip,
            path: options.path.clone(),
            port: options.port,
            version: options.version.clone(),
            uid: options.uid,
            gid: options.gid,
            msize: options.msize,
        }
    }

    /// Shell script that creates the mount point, mounts, and relaxes permissions.
    ///
    /// `mkdir` and `chmod` failures are ignored; only `mount` decides success.
    pub fn mount_command(&self) -> String {
        format!(
            "\nsudo mkdir -p {path} || true;\n\
             sudo mount -t 9p -o trans=tcp,port={port},dfltuid={uid},dfltgid={gid},version={version},msize={msize} {ip} {path};\n\
             sudo chmod 775 {path} || true;",
            path = self.path,
            port = self.port,
            uid = self.uid,
            gid = self.gid,
            version = self.version,
            msize = self.msize,
            ip = self.ip,
        )
    }
}

/// Best-effort unmount of `path`.
pub fn unmount_command(path: &str) -> String {
    format!("sudo umount {};", path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> MountSpec {
        let options = MountOptions {
            path: "/mnt/x".to_string(),
            port: 5000,
            version: "9p2000.L".to_string(),
            uid: 1000,
            gid: 1000,
            msize: 262144,
        };
        MountSpec::new("10.0.0.2".parse().unwrap(), &options)
    }

    #[test]
    fn test_mount_command_shape() {
        let cmd = spec().mount_command();

        assert_eq!(cmd.matches("mkdir").count(), 1);
        assert_eq!(cmd.matches("sudo mount ").count(), 1);
        assert_eq!(cmd.matches("chmod 775").count(), 1);
        assert!(cmd.contains("sudo mkdir -p /mnt/x || true;"));
        assert!(cmd.contains(
            "mount -t 9p -o trans=tcp,port=5000,dfltuid=1000,dfltgid=1000,version=9p2000.L,msize=262144 10.0.0.2 /mnt/x;"
        ));
        assert!(cmd.contains("sudo chmod 775 /mnt/x || true;"));
    }

    #[test]
    fn test_mount_command_is_exact() {
        assert_eq!(
            spec().mount_command(),
            "\nsudo mkdir -p /mnt/x || true;\n\
             sudo mount -t 9p -o trans=tcp,port=5000,dfltuid=1000,dfltgid=1000,version=9p2000.L,msize=262144 10.0.0.2 /mnt/x;\n\
             sudo chmod 775 /mnt/x || true;"
        );
    }

    #[test]
    fn test_unmount_command() {
        assert_eq!(unmount_command("/mnt/x"), "sudo umount /mnt/x;");
    }

    #[test]
    fn test_mount_options_defaults() {
        let options = MountOptions::new("/data", 4000);
        assert_eq!(options.version, "9p2000.L");
        assert_eq!(options.msize, 262144);
        assert_eq!(options.uid, 1001);
    }
}
