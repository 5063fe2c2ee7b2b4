use zkattest::algorithm::AlgorithmRegistry;
use zkattest::wire::SERVICE_ID;

/// Display version information
pub fn execute() {
    println!("zkattest {}", env!("CARGO_PKG_VERSION"));
    println!("Attribute attestation node with zero-knowledge verification");
    println!("Service id: {}", SERVICE_ID);
    println!(
        "Identity formats: {}",
        AlgorithmRegistry::with_defaults().formats().join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_execute() {
        // Version command should not panic
        execute();
    }
}
