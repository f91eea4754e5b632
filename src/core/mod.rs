pub mod anomaly;
pub mod column;
pub mod column_pool;
pub mod pipeline;
pub mod sequence_memory;
pub mod synapses;
pub mod topology;
