pub mod client;
pub mod error;
pub mod mapper;
pub mod phone;
pub mod photo;
pub mod types;

pub use client::{ConnectionReport, PrpClient};
pub use error::{ErrorKind, PrpError, PrpResult};
pub use types::{EmployeeRecord, PrpDepartment, PrpEmployee, RejectedEmployee};
