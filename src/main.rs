fn main() {
    macroweave::cli::run();
}
