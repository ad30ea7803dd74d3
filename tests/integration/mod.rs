//! End-to-end scenarios across the promptc crates

mod compile_flow;
mod judge_metric;
mod openai_compile;
mod serving_flow;
