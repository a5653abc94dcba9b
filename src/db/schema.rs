pub const SCHEMA: &str = r#"
-- Folders: one row per directory level below a library root
CREATE TABLE IF NOT EXISTS folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    parent_id INTEGER,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (parent_id) REFERENCES folders(id) ON DELETE CASCADE
);

-- Sibling names are unique; root names are unique among roots
CREATE UNIQUE INDEX IF NOT EXISTS idx_folders_child ON folders(parent_id, name) WHERE parent_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_folders_root ON folders(name) WHERE parent_id IS NULL;

CREATE TABLE IF NOT EXISTS folder_groups (
    folder_id INTEGER NOT NULL,
    access TEXT NOT NULL,  -- 'view' or 'edit'
    group_name TEXT NOT NULL,
    PRIMARY KEY (folder_id, access, group_name),
    FOREIGN KEY (folder_id) REFERENCES folders(id) ON DELETE CASCADE
);

-- Rough dates: a date known to the year, month or day
CREATE TABLE IF NOT EXISTS rough_dates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    month_valid INTEGER NOT NULL,
    day_valid INTEGER NOT NULL,
    UNIQUE (date, month_valid, day_valid),
    CHECK (day_valid = 0 OR month_valid = 1)
);

-- Rough locations: absent parts are NULL, never empty strings
CREATE TABLE IF NOT EXISTS rough_locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    country TEXT NOT NULL,
    subdivision TEXT,
    city TEXT,
    sub_location TEXT
);

-- NULL-aware uniqueness: NUL cannot appear in a stored value, so it marks absence
CREATE UNIQUE INDEX IF NOT EXISTS idx_rough_locations_key ON rough_locations(
    country,
    IFNULL(subdivision, char(0)),
    IFNULL(city, char(0)),
    IFNULL(sub_location, char(0))
);

CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- Images: one row per unique file content
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL UNIQUE,
    perceptual_hash TEXT,
    original_path TEXT NOT NULL UNIQUE,
    file_size INTEGER NOT NULL,

    width INTEGER NOT NULL DEFAULT 0,
    height INTEGER NOT NULL DEFAULT 0,
    thumbnail_width INTEGER NOT NULL DEFAULT 0,
    thumbnail_height INTEGER NOT NULL DEFAULT 0,
    large_width INTEGER NOT NULL DEFAULT 0,
    large_height INTEGER NOT NULL DEFAULT 0,
    orientation INTEGER,

    title TEXT,
    description TEXT,

    folder_id INTEGER NOT NULL,
    source_id INTEGER,
    location_id INTEGER,
    date_id INTEGER,

    dirty INTEGER NOT NULL DEFAULT 0,
    starred INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

    FOREIGN KEY (folder_id) REFERENCES folders(id),
    FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE SET NULL,
    FOREIGN KEY (location_id) REFERENCES rough_locations(id),
    FOREIGN KEY (date_id) REFERENCES rough_dates(id)
);

CREATE INDEX IF NOT EXISTS idx_images_folder ON images(folder_id);
CREATE INDEX IF NOT EXISTS idx_images_dirty ON images(dirty);
CREATE INDEX IF NOT EXISTS idx_images_deleted ON images(deleted_at);

CREATE TABLE IF NOT EXISTS image_groups (
    image_id INTEGER NOT NULL,
    access TEXT NOT NULL,
    group_name TEXT NOT NULL,
    PRIMARY KEY (image_id, access, group_name),
    FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE
);

-- People and pets named in image regions
CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS person_groups (
    person_id INTEGER NOT NULL,
    access TEXT NOT NULL,
    group_name TEXT NOT NULL,
    PRIMARY KEY (person_id, access, group_name),
    FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS pets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS pet_groups (
    pet_id INTEGER NOT NULL,
    access TEXT NOT NULL,
    group_name TEXT NOT NULL,
    PRIMARY KEY (pet_id, access, group_name),
    FOREIGN KEY (pet_id) REFERENCES pets(id) ON DELETE CASCADE
);

-- Bounding boxes are normalized: center x/y, width, height in [0, 1]
CREATE TABLE IF NOT EXISTS person_in_image (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_id INTEGER NOT NULL,
    person_id INTEGER NOT NULL,
    center_x REAL NOT NULL,
    center_y REAL NOT NULL,
    width REAL NOT NULL,
    height REAL NOT NULL,
    description TEXT,
    exclude_from_training INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE,
    FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_person_in_image_image ON person_in_image(image_id);

CREATE TABLE IF NOT EXISTS pet_in_image (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_id INTEGER NOT NULL,
    pet_id INTEGER NOT NULL,
    center_x REAL NOT NULL,
    center_y REAL NOT NULL,
    width REAL NOT NULL,
    height REAL NOT NULL,
    description TEXT,
    FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE,
    FOREIGN KEY (pet_id) REFERENCES pets(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_pet_in_image_image ON pet_in_image(image_id);

-- Hierarchical tags from keyword trees
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    parent_id INTEGER,
    FOREIGN KEY (parent_id) REFERENCES tags(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_child ON tags(parent_id, name) WHERE parent_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_root ON tags(name) WHERE parent_id IS NULL;

-- applied = 0 for structural ancestors that were not asserted themselves
CREATE TABLE IF NOT EXISTS tag_on_image (
    image_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    applied INTEGER NOT NULL,
    PRIMARY KEY (image_id, tag_id),
    FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tag_on_image_tag ON tag_on_image(tag_id);

-- Scan history
CREATE TABLE IF NOT EXISTS scans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    roots TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    completed_at TEXT,
    files_found INTEGER DEFAULT 0,
    files_new INTEGER DEFAULT 0,
    files_moved INTEGER DEFAULT 0,
    files_changed INTEGER DEFAULT 0,
    files_unchanged INTEGER DEFAULT 0,
    files_failed INTEGER DEFAULT 0,
    status TEXT DEFAULT 'running'  -- 'running', 'completed', 'failed'
);
"#;

/// Column additions for catalogs created by older versions. Each statement
/// may fail on an up-to-date catalog; failures are ignored.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE images ADD COLUMN starred INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE person_in_image ADD COLUMN exclude_from_training INTEGER NOT NULL DEFAULT 0",
];
