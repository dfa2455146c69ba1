pub mod evaluator;
pub mod gate;

pub use evaluator::PriceChangeEvaluator;
pub use gate::AlertGate;
