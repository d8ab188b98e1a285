pub mod file_display_surface;
