fn main() -> anyhow::Result<()> {
    waitbench::run()
}
