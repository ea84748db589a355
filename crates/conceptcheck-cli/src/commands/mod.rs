pub mod analyze;
pub mod compare;
pub mod evaluate;
pub mod init;
pub mod overview;
pub mod validate;
