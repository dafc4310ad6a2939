pub mod tenant;

pub use tenant::{RequireTenant, ResolvedTenant, TENANT_SLUG_HEADER};
