use std::env;
use std::process;

fn main() {
    let mut args = env::args();
    let _bin = args.next();
    let Some(path) = args.next() else {
        eprintln!("usage: scenario_eval <scenario.json>");
        process::exit(2);
    };

    match panofish_eval::evaluate_scenario_path(&path) {
        Ok(report) => {
            println!("scenario: {}", report.scenario_name);
            println!(
                "frames: {} ({} delivered, {} dropped)",
                report.frame_count, report.delivered_frames, report.dropped_frames
            );
            println!("non-black ratio min: {:.4}", report.min_non_black_ratio);
            println!("non-black ratio mean: {:.4}", report.mean_non_black_ratio);
            println!("retained area mean: {:.4}", report.mean_retained_area);
            println!("frames needing review: {}", report.review_frames);
            if report.failures.is_empty() {
                println!("status: PASS");
                process::exit(0);
            }

            println!("status: FAIL");
            for failure in report.failures {
                println!("- {}", failure);
            }
            process::exit(1);
        }
        Err(err) => {
            eprintln!("evaluation failed: {err}");
            process::exit(1);
        }
    }
}
