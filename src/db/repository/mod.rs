pub mod appointment;
pub mod brand;
pub mod customer;
pub mod customer_metric;
pub mod job_queue;
pub mod stats;

pub use appointment::AppointmentRepository;
pub use brand::{BrandRepository, LocationRepository, StaffRepository};
pub use customer::CustomerRepository;
pub use customer_metric::{CompletionApply, CustomerMetricRepository};
pub use job_queue::JobQueueRepository;
pub use stats::StatsRepository;
