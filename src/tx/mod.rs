pub mod command;
pub mod validation;

pub use command::{booking_id_for, BookingRequest, Command, CommandKind};
pub use validation::{
    compute_tokens, validate, validate_booking, validate_submit_booking, validate_transition,
    BookingDraft, ValidationContext,
};
