//! Sample choreographies for choreo-epp
//!
//! Two small protocols that exercise every primitive of the engine:
//!
//! - [`bookseller`]: a buyer asks a seller for a book's price and decides
//!   whether to buy it within budget
//! - [`parking`]: a ticketer, a parking authority and a printer cooperate to
//!   ticket every expired space in a garage

pub mod bookseller;
pub mod parking;

pub use bookseller::{run_bookseller, BooksellerChoreography, Outcome, BUYER, SELLER};
pub use parking::{
    run_parking, Clock, FixedClock, Garage, ParkingSpace, SystemClock, Ticket,
    TicketingChoreography, PARKING_AUTHORITY, PRINTER, TICKETER,
};
