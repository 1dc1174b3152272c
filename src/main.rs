fn main() {
    causerie::cli::main();
}
