use std::env;

fn main() {
    // Release pipelines stamp the commit date; local builds fall back to `unknown`
    let commit_date = env::var("MACOS_UTILS_COMMIT_DATE").unwrap_or_else(|_| "unknown".into());

    println!("cargo:rustc-env=MACOS_UTILS_COMMIT_DATE={commit_date}");
    println!("cargo:rerun-if-env-changed=MACOS_UTILS_COMMIT_DATE");
}
