// Build-time validation of the metric and label name patterns
use regex::Regex;
use std::fs::File;
use std::io::Write;

/// Prometheus-compatible name patterns, shared with `src/domain/validation.rs`.
const PATTERNS: &[(&str, &str)] = &[
    (r#"^[a-zA-Z_:][a-zA-Z0-9_:]*$"#, "metric_name"),
    (r#"^[a-zA-Z_][a-zA-Z0-9_]*$"#, "label_name"),
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let mut invalid_patterns = Vec::new();

    for &(pattern, name) in PATTERNS {
        if let Err(e) = Regex::new(pattern) {
            println!("cargo:warning=Invalid regex pattern '{}': {}", name, e);
            invalid_patterns.push((pattern, name, e));
        }
    }

    if !invalid_patterns.is_empty() {
        let mut error_msg = String::from("Build failed due to invalid name patterns:\n");
        for (pattern, name, error) in &invalid_patterns {
            error_msg.push_str(&format!("  - '{}': {} (pattern: {})\n", name, error, pattern));
        }
        panic!("{}", error_msg);
    }

    if let Err(e) = generate_validated_patterns(PATTERNS) {
        panic!("Failed to generate name patterns: {}", e);
    }
}

fn generate_validated_patterns(patterns: &[(&str, &str)]) -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::env::var("OUT_DIR")?;
    let dest_path = std::path::Path::new(&out_dir).join("validated_patterns.rs");
    let mut file = File::create(dest_path)?;

    writeln!(file, "// Auto-generated name patterns (validated by build.rs)")?;
    for (pattern, name) in patterns {
        writeln!(file, "pub const {}_PATTERN: &str = r#\"{}\"#;", name.to_uppercase(), pattern)?;
    }

    Ok(())
}
