// libs/scheduling-cell/src/services/mod.rs

pub mod booking;
pub mod conflict;
pub mod generator;
pub mod lifecycle;
pub mod payment;
pub mod slots;

pub use booking::AppointmentBookingService;
pub use conflict::ConflictDetectionService;
pub use generator::SlotGenerator;
pub use lifecycle::AppointmentLifecycleService;
pub use payment::PaymentVerificationService;
pub use slots::TimeSlotService;
