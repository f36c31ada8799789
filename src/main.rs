use octa_trace::{EngineConfig, OctaResult};

fn main() -> OctaResult<()> {
    octa_trace::run(EngineConfig::default())
}
