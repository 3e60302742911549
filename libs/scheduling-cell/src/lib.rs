// libs/scheduling-cell/src/lib.rs
//! # Scheduling Cell
//!
//! This cell owns the clinic calendar: generating bookable time slots,
//! claiming them for appointments, and walking appointments through
//! their lifecycle.
//!
//! ## Features
//!
//! - **Slot Generation**: Back-to-back slots from service durations, per day or in bulk
//! - **Concurrency-safe Booking**: Conditional status flips, no read-then-write races
//! - **Appointment Lifecycle**: pending -> confirmed -> completed, with cancellation
//! - **Conflict Detection**: Half-open interval overlap checks for ad-hoc bookings
//! - **Payment Gate**: Optional payment-intent verification before creation
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                 Scheduling Cell                     |
//! +-----------------------------------------------------+
//! |  handlers.rs    |  HTTP endpoint handlers           |
//! |  router.rs      |  Route definitions                |
//! |  models.rs      |  Data structures & DTOs           |
//! |  services/      |  Business logic layer             |
//! |    generator.rs |  Candidate slot arithmetic        |
//! |    conflict.rs  |  Overlap detection                |
//! |    slots.rs     |  Slot storage & release           |
//! |    lifecycle.rs |  Appointment state machine        |
//! |    booking.rs   |  Booking coordination             |
//! |    payment.rs   |  Payment gateway client           |
//! +-----------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! ### Time Slots
//! - `GET /time-slots/available` - List open slots for a day
//! - `POST /time-slots` - Create a single slot (admin)
//! - `POST /time-slots/generate` - Generate a day for one service (admin)
//! - `POST /time-slots/generate-all` - Generate a date range for all services (admin)
//! - `POST /time-slots/book` - Claim a slot for an appointment
//! - `POST /time-slots/release` - Free a booked slot (admin)
//! - `PUT /time-slots/{id}` - Reschedule or relabel a slot (admin)
//! - `DELETE /time-slots/{id}` - Remove an unbooked slot (admin)
//!
//! ### Appointments
//! - `POST /appointments` - Create a pending appointment
//! - `GET /appointments/me` - List the caller's appointments
//! - `GET /appointments/{id}` - Fetch one appointment
//! - `PUT /appointments/me/{id}/cancel` - Cancel (frees a linked slot)
//! - `PUT /appointments/{id}/complete` - Mark completed (admin)

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

// Re-export commonly used types
pub use models::{
    Appointment, AppointmentStatus, BookSlotRequest, BookSlotResponse,
    CreateAppointmentRequest, CreateTimeSlotRequest, GenerateAllSlotsRequest,
    GenerateSlotsRequest, GenerationSummary, SchedulingError, Service, SlotStatus, TimeSlot,
};

pub use services::{
    AppointmentBookingService, AppointmentLifecycleService, ConflictDetectionService,
    PaymentVerificationService, SlotGenerator, TimeSlotService,
};

pub use router::{appointment_routes, time_slot_routes};
