fn main() {
    forkchat_lib::run();
}
