use std::env;

/// Default bootloader start address, must match `config::BOOT_START`.
const DEFAULT_BOOT_START: &str = "0x1A40";

fn main() {
    println!("cargo:rerun-if-env-changed=USI_TWI_BOOT_START");

    // Host builds only carry the library and its simulation tests
    let target = env::var("TARGET").unwrap_or_default();
    if !target.contains("avr") {
        return;
    }

    let boot_start =
        env::var("USI_TWI_BOOT_START").unwrap_or_else(|_| DEFAULT_BOOT_START.to_string());

    // Configure for ATtiny85
    println!("cargo:rustc-link-arg=-mmcu=attiny85");

    // The bootloader is linked at the top of flash, above the application
    println!("cargo:rustc-link-arg=-Wl,--section-start=.text={}", boot_start);
    println!("cargo:rustc-env=USI_TWI_BOOT_START={}", boot_start);

    if env::var("PROFILE").map(|p| p == "debug").unwrap_or(false) {
        println!("cargo:warning=Debug bootloader builds may not fit below the application area");
    }
}
