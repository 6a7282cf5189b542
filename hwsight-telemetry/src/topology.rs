//! Topology synthesized from processor counts, for platforms that only
//! report totals.

use hwsight_common::model::LogicalProcessor;

/// Spread `logical` processors evenly over `physical` cores and `packages`
/// sockets. Zero counts are treated as one.
pub fn synthesize_topology(logical: u32, physical: u32, packages: u32) -> Vec<LogicalProcessor> {
    let logical = logical.max(1);
    let physical = physical.clamp(1, logical);
    let packages = packages.clamp(1, physical);
    (0..logical)
        .map(|n| {
            let core = n * physical / logical;
            LogicalProcessor {
                processor_number: n,
                physical_processor_number: core,
                physical_package_number: core * packages / physical,
                numa_node: 0,
            }
        })
        .collect()
}
