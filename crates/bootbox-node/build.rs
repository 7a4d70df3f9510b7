use vergen_gitcl::{BuildBuilder, CargoBuilder, Emitter, GitclBuilder, RustcBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let build = BuildBuilder::default().build_timestamp(true).build()?;
    let cargo = CargoBuilder::default().target_triple(true).build()?;
    let rustc = RustcBuilder::default().semver(true).build()?;
    let git = GitclBuilder::default().sha(true).dirty(true).build();

    let mut emitter = Emitter::default();
    emitter
        .add_instructions(&build)?
        .add_instructions(&cargo)?
        .add_instructions(&rustc)?;

    // Outside a checkout (release tarballs) take git info from the environment
    if let Ok(git) = git {
        emitter.add_instructions(&git)?;
    } else {
        for (key, fallback) in [("VERGEN_GIT_SHA", "unknown"), ("VERGEN_GIT_DIRTY", "false")] {
            println!(
                "cargo::rustc-env={key}={}",
                std::env::var(key).unwrap_or_else(|_| fallback.to_string())
            );
        }
    }

    emitter.emit()?;
    Ok(())
}
