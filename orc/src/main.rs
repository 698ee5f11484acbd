fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(error) => liborc::error::report_error_and_exit(&error),
    }
}

fn run() -> liborc::error::Result<i32> {
    let args = liborc::Args::parse(std::env::args().skip(1))?;
    liborc::run(&args)
}
