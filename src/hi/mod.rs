pub mod assembler;
pub mod cgi;
pub mod handler;
pub mod response;
pub mod service;
