fn main() {
    println!("cargo:rerun-if-env-changed=ANYOS_ASM_OBJECTS");
    if let Ok(objects) = std::env::var("ANYOS_ASM_OBJECTS") {
        for obj in objects.split(',') {
            let obj = obj.trim();
            if !obj.is_empty() {
                println!("cargo:rustc-link-arg={}", obj);
                println!("cargo:rerun-if-changed={}", obj);
            }
        }
    }

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    println!("cargo:rustc-link-arg=-T{}/link.ld", manifest_dir);
    println!("cargo:rerun-if-changed=link.ld");
}
