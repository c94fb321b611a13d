use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=PIPELINE_GIT_SHA");

    if std::env::var("PIPELINE_GIT_SHA").is_ok() {
        return;
    }

    let sha = match Command::new("git").args(["rev-parse", "HEAD"]).output() {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        Ok(out) => {
            eprintln!("cargo:warning=git rev-parse failed with {}, git_sha will be 'unknown'", out.status);
            return;
        }
        Err(e) => {
            eprintln!("cargo:warning=git not found ({e}), git_sha will be 'unknown'");
            return;
        }
    };

    if !sha.is_empty() {
        println!("cargo:rustc-env=PIPELINE_GIT_SHA={sha}");
    }
}
