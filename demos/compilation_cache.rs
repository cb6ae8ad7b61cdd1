//! A worked demonstration of `memocache`: a toy "optimization pass" over a
//! list of integers, memoized by its input and a target-triple environment
//! descriptor.

use memocache::canon::{CanonValue, Canonicalize};
use memocache::{Cache, CacheConfig, Operation, OperationFingerprint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OptimizedProgram {
    instructions: Vec<i64>,
}

impl Canonicalize for OptimizedProgram {
    fn to_canon(&self) -> CanonValue {
        self.instructions.to_canon()
    }
}

#[derive(Debug, Error)]
#[error("optimization pass failed: {0}")]
struct OptimizeError(String);

struct ConstantFold;

impl Operation for ConstantFold {
    type Args = (Vec<i64>,);
    type Output = OptimizedProgram;
    type Error = OptimizeError;

    fn call(&self, args: &Self::Args) -> Result<Self::Output, Self::Error> {
        // Stand-in "expensive" pass: drop adjacent zero-additions.
        let folded = args.0.iter().copied().filter(|&x| x != 0).collect();
        Ok(OptimizedProgram { instructions: folded })
    }

    fn fingerprint(&self) -> OperationFingerprint {
        OperationFingerprint {
            qualified_name: "demos::compilation_cache::ConstantFold".to_string(),
            source: "drop adjacent zero-additions".to_string(),
        }
    }
}

fn main() {
    let config = CacheConfig::from_env("compilation-cache-demo");
    let cache = Cache::open(ConstantFold, &"x86_64-unknown-linux-gnu", config)
        .expect("failed to open demo cache");

    let program = vec![1, 0, 2, 0, 3];
    let first = cache.call(&(program.clone(),)).expect("first call");
    println!("first call result: {:?}", first);

    let second = cache.call(&(program,)).expect("second call (should be a hit)");
    println!("second call result: {:?}", second);
}
