// Application layer: the two pipelines wired from ports, layouts and the merge/filter core.

pub mod pipelines;
