fn main() {
    if let Err(err) = union_views::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
