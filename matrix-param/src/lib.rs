pub mod bundle;
pub mod ndarray_beta;
pub mod ndarray_gaussian;
pub mod ndarray_spike_slab;
pub mod pair;
pub mod traits;
