use pprof_parse::Profile;
use std::env;
use std::fs::File;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <profile.pb.gz>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    match Profile::parse(file) {
        Ok(profile) => {
            println!("Valid pprof profile: {}", path);
            for sample_type in &profile.sample_types {
                println!("  Sample type: {}/{}", sample_type.kind, sample_type.unit);
            }
            println!("  Samples: {}", profile.samples.len());
            println!("  Locations: {}", profile.locations.len());
            println!("  Functions: {}", profile.functions.len());
            let total: i64 = profile
                .samples
                .iter()
                .filter_map(|s| s.values.first())
                .sum();
            println!("  Total value: {}", total);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid pprof profile '{}': {}", path, e);
            ExitCode::FAILURE
        }
    }
}
