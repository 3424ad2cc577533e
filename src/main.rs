fn main() {
    #[cfg(feature = "cli")]
    refdelta::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("refdelta: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
