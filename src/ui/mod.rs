pub mod chat_loop;
pub mod render_units;
pub mod renderer;
