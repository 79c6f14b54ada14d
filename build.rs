// The parser and code generator recurse once per binary operator, so long
// right-nested expressions need more native stack than the platform default.
const STACK_SIZE: u64 = 128 * 1024 * 1024;

fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();

    let link_arg = match (target_os.as_str(), target_env.as_str()) {
        ("windows", "msvc") => format!("/STACK:{}", STACK_SIZE),
        ("windows", "gnu") => format!("-Wl,--stack,{}", STACK_SIZE),
        ("linux", _) => format!("-Wl,-z,stack-size={}", STACK_SIZE),
        ("macos", _) => format!("-Wl,-stack_size,{:#x}", STACK_SIZE),
        _ => return,
    };
    println!("cargo:rustc-link-arg-bin=mypl={}", link_arg);
}
