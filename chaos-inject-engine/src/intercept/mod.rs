pub mod access;
pub mod response;
pub mod route;
