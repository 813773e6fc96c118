//! Quantization step control: the closed rate loop and the perceptual table

pub mod perceptual;
pub mod rate;

pub use perceptual::{compute_step_table, step_table_for_layout, threshold_of_hearing};
pub use rate::{
    ConservativeExponential, ControlLaw, CounterSnapshot, LossAdditive, RateController,
    RateControllerHandle, RateCounters, RateDecision, RateLaw, RateState, StepBounds,
    TargetBitrate,
};
