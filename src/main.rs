fn main() -> std::process::ExitCode {
    barcode_inventory_lib::run()
}
