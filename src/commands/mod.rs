pub mod init;
pub mod run_once;
pub mod serve;
pub mod status;
