//! Route handlers. Every JSON body uses [`response::ApiResponse`].

pub mod add_doctor;
pub mod health;
pub mod login;
pub mod register;
pub mod response;
pub mod root;
pub mod session;
