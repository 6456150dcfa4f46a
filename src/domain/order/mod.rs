// ============================================================================
// Order Domain
// ============================================================================
//
// - Value objects (ProductItem, OrderStatus)
// - Events (OrderCreated, OrderPaid, ...) and the closed EventType set
// - Commands and business rule errors
// - Aggregate (Order) and the transactional command handler
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
