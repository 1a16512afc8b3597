use std::env;

use driver_catalog::{default_query, MetadataExtractor};

fn main() {
    // Use: demo <file>
    // Example: demo 'C:\Windows\System32\CatRoot\{F750E6C3-38EE-11D1-85E5-00C04FC295EE}\oem42.cat'
    let path = env::args().nth(1).expect("usage: demo <file>");
    let extractor = MetadataExtractor::new(default_query());

    let entries = extractor
        .extract(&path)
        .expect("failed to read catalog metadata");

    for entry in &entries {
        println!("{}\t{}", entry.key, entry.value);
    }
}
