// Linux platform implementations

#[cfg(target_os = "linux")]
pub mod screen_x11;
#[cfg(target_os = "linux")]
pub mod screen;

// Pixel conversion is display-independent
pub mod pixels;
