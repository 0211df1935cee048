mod cursor;
mod reader;

pub use cursor::Cursor;
pub use reader::Reader;
