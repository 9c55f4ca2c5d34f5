//! Order admission: advisory stock evaluation and the transactional commit.

pub mod evaluator;
pub mod order_admission;

pub use evaluator::{Reservation, ReservationEvaluator, ReservationSource};
pub use order_admission::OrderAdmission;
