fn main() -> anyhow::Result<()> {
    moodplay_lib::run()
}
