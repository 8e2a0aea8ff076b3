fn main() {
    // Recompile when the baked-in endpoint changes; option_env!() values are
    // otherwise cached.
    println!("cargo:rerun-if-env-changed=TELEMETRY_DEFAULT_ENDPOINT");
}
