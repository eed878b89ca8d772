// Common tools shared by the transport and middleware

pub mod headers;
pub mod once;
pub mod routes;
