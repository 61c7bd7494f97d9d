//! Arch command implementation

use imxflash_core::arch;

/// Show the machine type and the label derived from it
pub fn run_arch() -> Result<(), Box<dyn std::error::Error>> {
    let mut machine = None;
    let label = arch::detect_with(|| {
        let raw = arch::query_machine()?;
        machine = Some(raw.clone());
        Ok(raw)
    });

    match &machine {
        Some(machine) => println!("Machine type:     {}", machine),
        None => println!("Machine type:     (unavailable)"),
    }
    println!("Architecture:     {}", label);
    if label.is_known() {
        println!("Passed to script: yes (-a {})", label);
    } else {
        println!("Passed to script: no");
    }

    Ok(())
}
