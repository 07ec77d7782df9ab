pub mod generator;

pub use generator::{
    generate, AllocationPolicy, GenerationResult, GeneratorContext,
};
