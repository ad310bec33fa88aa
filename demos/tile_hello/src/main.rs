use std::time::Instant;

use tile_sort::*;

const LEN: usize = 100_000;

fn main() -> Result<()> {
    println!("=== Tile Primitives Pipeline ===\n");

    let config = LaunchConfig::from_env()?;
    print_config_info(&config);

    let data: Vec<u64> = (0..LEN as u64)
        .map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 44)
        .collect();
    println!("Step 1: Generated {} elements", data.len());

    // --- Reduce ---
    let start = Instant::now();
    let sum = reduce_execute::<256, _>(&data, &config)?;
    let expected: u64 = data.iter().sum();
    println!(
        "Step 2: reduce    = {sum} ({:?}) {}",
        start.elapsed(),
        verdict(sum == expected)
    );

    // --- Scan ---
    let mut prefix = data.clone();
    let start = Instant::now();
    let total = scan_execute::<256, _>(&mut prefix, &config)?;
    let ok = total == expected
        && prefix[0] == 0
        && prefix.windows(2).zip(&data).all(|(w, x)| w[1] == w[0] + x);
    println!("Step 3: scan      = {total} ({:?}) {}", start.elapsed(), verdict(ok));

    // --- Partition ---
    let pivot = 1 << 19;
    let mut parts = data.clone();
    let start = Instant::now();
    let split = partition_execute::<256, _, _>(&mut parts, |x| *x < pivot, &config)?;
    let ok = split == data.iter().filter(|&&x| x < pivot).count()
        && parts[..split].iter().all(|&x| x < pivot)
        && parts[split..].iter().all(|&x| x >= pivot);
    println!(
        "Step 4: partition split at {split} of {} ({:?}) {}",
        parts.len(),
        start.elapsed(),
        verdict(ok)
    );

    println!("\n=== Pipeline complete ===");
    Ok(())
}

/// Print the launch configuration picked from the environment.
fn print_config_info(config: &LaunchConfig) {
    println!("  Backend:          {}", config.backend);
    println!(
        "  Forward progress: {}",
        config.backend.guarantees_forward_progress()
    );
    println!("  Partition:        {}", config.partition);
    println!("  Max resident:     {} tiles", config.max_resident_tiles);
    println!();
}

fn verdict(ok: bool) -> &'static str {
    if ok {
        "[OK]"
    } else {
        "[MISMATCH]"
    }
}
