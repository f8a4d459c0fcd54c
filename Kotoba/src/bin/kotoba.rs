fn main() -> anyhow::Result<()> {
    kotoba::cli::run_cli()
}
