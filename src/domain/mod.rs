// Domain layer: records, cell values and the ports the pipelines talk through.

pub mod model;
pub mod ports;
