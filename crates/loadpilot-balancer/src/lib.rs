//! loadpilot-balancer — request routing across components.
//!
//! Filters the registered components down to healthy candidates for a
//! request, then picks one with the active algorithm. The optimizer
//! tracks how each algorithm performs and switches the active one when
//! another has proven better.
//!
//! # Architecture
//!
//! ```text
//! LoadBalancer
//!   ├── CapacityRegistry + MetricsStore (read-only snapshot per selection)
//!   ├── candidate filter (status, health, avoid/prefer lists)
//!   ├── strategy (pure scoring over the candidate snapshot)
//!   │     round robin · weighted round robin · least connections ·
//!   │     least response time · resource · performance · adaptive
//!   └── per-algorithm performance counters (all-time and a rolling window)
//!
//! AlgorithmOptimizer (background loop)
//!   ├── samples load distribution for the active algorithm
//!   └── switches to the best-scoring algorithm with enough samples
//! ```

pub mod balancer;
pub mod optimizer;
pub mod round_robin;
pub mod strategy;

pub use balancer::{LoadBalancer, Selection};
pub use optimizer::AlgorithmOptimizer;
pub use round_robin::WorkloadCursors;
pub use strategy::{Candidate, WeightedTickets};
