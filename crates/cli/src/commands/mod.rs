pub mod dependencies;
pub mod init;
