use std::env;
use std::fs;

use tilebench_types::{MatmulSuite, ReductionSuite, SuiteSet};

fn read_suite(manifest_dir: &str, name: &str) -> String {
    let path = format!("{}/suites/{}", manifest_dir, name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e))
}

fn main() {
    println!("cargo:rerun-if-changed=suites/matmul.json");
    println!("cargo:rerun-if-changed=suites/reduction.json");

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();

    let matmul: Vec<MatmulSuite> = serde_json::from_str(&read_suite(&manifest_dir, "matmul.json"))
        .unwrap_or_else(|e| panic!("BUILD FAILED: matmul.json does not match MatmulSuite: {}", e));
    let reduction: Vec<ReductionSuite> =
        serde_json::from_str(&read_suite(&manifest_dir, "reduction.json")).unwrap_or_else(|e| {
            panic!("BUILD FAILED: reduction.json does not match ReductionSuite: {}", e)
        });

    for suite in &reduction {
        for v in &suite.variants {
            let factor = v.group[0] as usize * v.tile[0] as usize;
            let mut count = suite.count;
            for pass in 0..suite.passes {
                if factor == 0 || count % factor != 0 {
                    panic!(
                        "BUILD FAILED: {} ({}) pass {} sees {} elements, not divisible by {}",
                        v.label, suite.profile, pass + 1, count, factor
                    );
                }
                count /= factor;
            }
        }
    }

    let suites = SuiteSet { matmul, reduction };
    let binary = bincode::serialize(&suites).expect("Failed to serialize suites to bincode");
    fs::write(format!("{}/suites.bin", out_dir), binary).expect("Failed to write suites.bin");
}
