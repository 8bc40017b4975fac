use std::env;

fn main() {
    // 告诉 cargo 在 build.rs 变化时重新运行
    println!("cargo:rerun-if-changed=build.rs");

    // 主机测试构建不需要任何链接配置
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_arch != "xtensa" {
        return;
    }

    // esp-hal 1.0 自带 App Descriptor 与链接脚本
    println!("cargo:rustc-link-arg-bins=-Tlinkall.x");
}
