mod raop;
