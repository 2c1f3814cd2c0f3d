mod semantic;
